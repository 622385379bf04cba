fn main() {
    criuengine::main()
}
